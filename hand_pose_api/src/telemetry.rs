use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    detection_duration: Histogram<u64>,
    hands_detected: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("hand_pose_api");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let detection_duration = meter
            .u64_histogram("detection_duration_ms")
            .with_boundaries(detection_boundaries())
            .with_description("Duration of decode and detection in milliseconds")
            .build();

        let hands_detected = meter
            .u64_counter("hands_detected_total")
            .with_description("Total number of hands returned to clients")
            .build();

        Ok(Metrics {
            request_counter,
            detection_duration,
            hands_detected,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_detection_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.detection_duration.record(duration_ms, &attributes);
    }

    pub fn record_hands_detected(&self, count: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.hands_detected.add(count, &attributes);
    }
}

/// Buckets for `detection_duration_ms`: 5 ms steps up to 50 ms, where a
/// decode plus both model stages lands for one or two hands, then doubling
/// until past the default 10 s deadline.
fn detection_boundaries() -> Vec<f64> {
    let fine = (5..=50).step_by(5);
    let tail = std::iter::successors(Some(100u64), |&ms| Some(ms * 2))
        .take_while(|&ms| ms <= 12_800);

    fine.chain(tail).map(|ms| ms as f64).collect()
}
