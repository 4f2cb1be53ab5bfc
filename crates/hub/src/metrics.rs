use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

pub struct HubMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_duration_count: Mutex<HashMap<String, u64>>,
    ws_duration_sum_ms: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    ws_rate_total: Mutex<HashMap<String, u64>>,
    active_connections: AtomicU64,
    active_rooms: AtomicU64,
    active_sessions: AtomicU64,
    reaped_connections_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<HubMetrics>> = OnceLock::new();

impl Default for HubMetrics {
    fn default() -> Self {
        Self {
            request_duration_count: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_rate_total: Mutex::new(HashMap::new()),
            ws_duration_count: Mutex::new(HashMap::new()),
            ws_duration_sum_ms: Mutex::new(HashMap::new()),
            ws_errors_total: Mutex::new(HashMap::new()),
            ws_rate_total: Mutex::new(HashMap::new()),
            active_connections: AtomicU64::new(0),
            active_rooms: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            reaped_connections_total: AtomicU64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<HubMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<HubMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_ws_message(message_type: &str, is_error: bool, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_message(message_type, is_error, latency_ms);
    }
}

pub fn record_http_request(method: &str, path: &str, status_code: u16, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_http_request(method, path, status_code, latency_ms);
    }
}

pub fn set_active_connections(value: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.set_active_connections(value);
    }
}

pub fn set_active_rooms(value: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.set_active_rooms(value);
    }
}

pub fn set_active_sessions(value: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.set_active_sessions(value);
    }
}

pub fn increment_reaped_connections() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_reaped_connections();
    }
}

impl HubMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_ws_message(&self, message_type: &str, is_error: bool, latency_ms: u64) {
        let normalized = normalize_ws_message_type(message_type);
        increment_label_counter(&self.ws_rate_total, &normalized, 1);
        increment_label_counter(&self.ws_duration_sum_ms, &normalized, latency_ms);
        increment_label_counter(&self.ws_duration_count, &normalized, 1);
        if is_error {
            increment_label_counter(&self.ws_errors_total, &normalized, 1);
        }
    }

    pub fn set_active_connections(&self, value: u64) {
        self.active_connections.store(value, Ordering::SeqCst);
    }

    pub fn set_active_rooms(&self, value: u64) {
        self.active_rooms.store(value, Ordering::SeqCst);
    }

    pub fn set_active_sessions(&self, value: u64) {
        self.active_sessions.store(value, Ordering::SeqCst);
    }

    pub fn increment_reaped_connections(&self) {
        self.reaped_connections_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP hub_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE hub_request_rate_total counter\n");
        append_counter_lines(&mut output, "hub_request_rate_total", &self.request_rate_total);

        output.push_str("# HELP hub_request_errors_total Total HTTP error responses by endpoint.\n");
        output.push_str("# TYPE hub_request_errors_total counter\n");
        append_counter_lines(&mut output, "hub_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP hub_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE hub_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "hub_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP hub_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE hub_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "hub_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str("# HELP hub_ws_rate_total Total websocket messages by type.\n");
        output.push_str("# TYPE hub_ws_rate_total counter\n");
        append_label_counter_lines(&mut output, "hub_ws_rate_total", &self.ws_rate_total);

        output.push_str("# HELP hub_ws_errors_total Total websocket message errors by type.\n");
        output.push_str("# TYPE hub_ws_errors_total counter\n");
        append_label_counter_lines(&mut output, "hub_ws_errors_total", &self.ws_errors_total);

        output.push_str("# HELP hub_ws_duration_ms_sum Sum of websocket message latency in milliseconds by type.\n");
        output.push_str("# TYPE hub_ws_duration_ms_sum counter\n");
        append_label_counter_lines(&mut output, "hub_ws_duration_ms_sum", &self.ws_duration_sum_ms);

        output.push_str(
            "# HELP hub_ws_duration_ms_count Count of websocket latency samples by type.\n",
        );
        output.push_str("# TYPE hub_ws_duration_ms_count counter\n");
        append_label_counter_lines(&mut output, "hub_ws_duration_ms_count", &self.ws_duration_count);

        output.push_str("# HELP hub_active_connections Current number of live websocket connections.\n");
        output.push_str("# TYPE hub_active_connections gauge\n");
        output.push_str(&format!(
            "hub_active_connections {}\n",
            self.active_connections.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP hub_active_rooms Current number of rooms with at least one member.\n");
        output.push_str("# TYPE hub_active_rooms gauge\n");
        output
            .push_str(&format!("hub_active_rooms {}\n", self.active_rooms.load(Ordering::SeqCst)));

        output.push_str("# HELP hub_active_sessions Current number of collaboration sessions.\n");
        output.push_str("# TYPE hub_active_sessions gauge\n");
        output.push_str(&format!(
            "hub_active_sessions {}\n",
            self.active_sessions.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP hub_reaped_connections_total Total connections closed for inactivity.\n",
        );
        output.push_str("# TYPE hub_reaped_connections_total counter\n");
        output.push_str(&format!(
            "hub_reaped_connections_total {}\n",
            self.reaped_connections_total.load(Ordering::SeqCst)
        ));

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments = Vec::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if uuid::Uuid::parse_str(segment).is_ok() {
            normalized_segments.push("{uuid}".to_string());
            continue;
        }

        if segment.chars().all(|character| character.is_ascii_digit()) {
            normalized_segments.push("{number}".to_string());
            continue;
        }

        normalized_segments.push(segment.to_string());
    }

    if normalized_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", normalized_segments.join("/"))
    }
}

fn normalize_ws_message_type(message_type: &str) -> String {
    let normalized = message_type.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    if guard.is_empty() {
        return;
    }

    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{message_type=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
