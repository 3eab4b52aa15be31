pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# KUBECOST-OPTIMA CONFIGURATION
# =============================================================================
# Exports daily Kubecost allocation data as gzip-compressed CSV files and
# uploads them to Flexera Optima as one bill upload per invoice month.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/kubecost-optima/config.yml
#   3. /etc/kubecost-optima/config.yml
#
# Any value can reference an environment variable using the $env{...} syntax.

# =============================================================================
# KUBECOST
# =============================================================================
kubecost:
  # Base URL of the Kubecost model API (allocation endpoint is appended)
  base_url: http://localhost:9090/model/
  # Base URL used for getConfigs (defaults to base_url)
  # config_base_url: http://localhost:9090/

# =============================================================================
# FLEXERA OPTIMA
# =============================================================================
optima:
  org_id: "00000"
  bill_connect_id: cbi-oi-optima-kubecost
  # NAM, EU or AU
  shard: NAM
  # Credentials. When left out, REFRESH_TOKEN, SERVICE_APP_CLIENT_ID and
  # SERVICE_APP_CLIENT_SECRET are read from the environment.
  # refresh_token: <refresh token>
  # client_id: <service account client id>
  # client_secret: <service account client secret>
  create_bill_connect_if_not_exist: false
  vendor_name: Kubecost
  # Wait before retrying a rate-limited bill upload start
  rate_limit_backoff: 120s
  # Stale bill uploads aborted before a month gives up
  max_conflict_retries: 5

# =============================================================================
# EXPORT
# =============================================================================
export:
  output_dir: /var/kubecost
  # namespace, controller or pod
  aggregation: pod
  share_namespaces: kube-system,cadvisor
  idle: true
  idle_by_node: false
  share_idle: false
  share_tenancy_costs: true
  multiplier: 1.0
  # Delete files older than the start of the previous invoice month
  file_rotation: true
  include_previous_month: false
  max_file_rows: 1000000
  page_size: 500
  default_currency: USD
  override_pod_labels: false

# =============================================================================
# HTTP
# =============================================================================
http:
  request_timeout: 5m
"#
    .to_string()
}
