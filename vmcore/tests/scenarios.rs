//! Runs the engine's testable properties end to end against the mock
//! backend. Each test below is a thin wrapper around a scenario driver
//! from `vmcore-test-harness`, which owns the actual engine/source
//! wiring and assertions.

#[test]
fn sequence_cold_read() {
	vmcore_test_harness::run_s1().unwrap();
}

#[test]
fn large_object_stays_under_residency_budget() {
	vmcore_test_harness::run_s2().unwrap();
}

#[test]
fn binary_file_source_round_trips() {
	vmcore_test_harness::run_s3().unwrap();
}

#[test]
fn min_load_elements_is_honored() {
	vmcore_test_harness::run_s4().unwrap();
}

#[test]
fn lifecycle_returns_arena_to_starting_state() {
	vmcore_test_harness::run_s5().unwrap();
}

#[test]
fn populate_failure_installs_zero_page_and_records_error() {
	vmcore_test_harness::run_s6().unwrap();
}

#[test]
fn dirty_page_survives_eviction() {
	vmcore_test_harness::run_s7().unwrap();
}
