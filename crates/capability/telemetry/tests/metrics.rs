use wolf_telemetry::{metrics, record_delivery_ok, record_tick_skipped};

#[test]
fn counters_are_monotonic() {
    let before = metrics().snapshot();
    record_delivery_ok();
    record_delivery_ok();
    record_tick_skipped();
    let after = metrics().snapshot();
    assert!(after.deliveries_ok >= before.deliveries_ok + 2);
    assert!(after.ticks_skipped > before.ticks_skipped);
}

#[test]
fn init_tracing_is_idempotent() {
    wolf_telemetry::init_tracing("debug");
    wolf_telemetry::init_tracing("not a level");
}
