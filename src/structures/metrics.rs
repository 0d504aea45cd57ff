use prometheus::{opts, Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};

// Per-link registry; several links can live in one process
pub struct LinkMetrics {
    pub registry: Registry,
    pub bytes_in: IntCounter,
    pub bytes_out: IntCounter,
    pub data_events: IntCounter,
    pub connects: IntCounter,
    pub connect_failures: IntCounter,
    pub disconnects: IntCounterVec,
    pub connected: IntGauge,
}

impl LinkMetrics {
    pub fn new(link_id: &str) -> Self {
        let registry = Registry::new_custom(None, Some([("link_id".to_string(), link_id.to_string())].into()))
            .expect("create registry");

        let bytes_in = IntCounter::new("link_bytes_in_total", "Bytes received from the device")
            .expect("create counter");
        let bytes_out = IntCounter::new("link_bytes_out_total", "Bytes sent to the device")
            .expect("create counter");
        let data_events = IntCounter::new("link_data_events_total", "Data arrived notifications dispatched")
            .expect("create counter");
        let connects = IntCounter::new("link_connects_total", "Successful connects")
            .expect("create counter");
        let connect_failures = IntCounter::new("link_connect_failures_total", "Failed connect attempts")
            .expect("create counter");
        let disconnects = IntCounterVec::new(
            opts!("link_disconnects_total", "Connection endings by reason"),
            &["reason"],
        ).expect("create counter vec");
        let connected = IntGauge::new("link_connected", "1 while a connection is established")
            .expect("create gauge");

        registry.register(Box::new(bytes_in.clone())).expect("register counter");
        registry.register(Box::new(bytes_out.clone())).expect("register counter");
        registry.register(Box::new(data_events.clone())).expect("register counter");
        registry.register(Box::new(connects.clone())).expect("register counter");
        registry.register(Box::new(connect_failures.clone())).expect("register counter");
        registry.register(Box::new(disconnects.clone())).expect("register counter vec");
        registry.register(Box::new(connected.clone())).expect("register gauge");

        Self {
            registry,
            bytes_in,
            bytes_out,
            data_events,
            connects,
            connect_failures,
            disconnects,
            connected,
        }
    }

    pub fn disconnects_for(&self, reason: &str) -> u64 {
        self.disconnects.with_label_values(&[reason]).get()
    }

    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer).expect("encode metrics");
        String::from_utf8(buffer).unwrap_or_default()
    }
}
