//! Runtime configuration layering: defaults, config files, environment and
//! builder methods.

#[macro_use]
mod common;

use common::init_test_logging;
use strand::runtime::config::TimeSourceKind;
use strand::runtime::env_config::{ENV_INTERRUPTIBLE, ENV_START_TIME_MS, ENV_TIME_SOURCE, ENV_TRACE};
use strand::runtime::{RuntimeBuilder, RuntimeConfig};
use strand::{Effect, ErrorCategory, Time};

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

#[test]
fn builder_preset_flows_into_root_fibers() {
    init_test("builder_preset_flows_into_root_fibers");
    let runtime = RuntimeBuilder::deterministic()
        .start_time(Time::from_secs(1_000))
        .interruptible(false)
        .trace(false)
        .build()
        .expect("build");
    let config = runtime.config().clone();
    assert_with_log!(config.time_source == TimeSourceKind::Virtual, "virtual", "virtual", config.time_source);
    assert_with_log!(runtime.now() == Time::from_secs(1_000), "start time", Time::from_secs(1_000), runtime.now());

    let exit = runtime.block_on(Effect::<String, _>::get_runtime_flags()).expect("run");
    let flags = exit.expect("flags");
    assert_with_log!(!flags.interrupt_status, "uninterruptible roots", false, flags.interrupt_status);
    assert_with_log!(!flags.should_trace, "tracing off", false, flags.should_trace);
    test_complete!("builder_preset_flows_into_root_fibers");
}

#[test]
fn env_layer_sits_between_base_config_and_builder_methods() {
    init_test("env_layer_sits_between_base_config_and_builder_methods");
    // The only test in this binary that touches the environment.
    std::env::set_var(ENV_TIME_SOURCE, "virtual");
    std::env::set_var(ENV_START_TIME_MS, "2500");
    std::env::set_var(ENV_TRACE, "off");
    std::env::remove_var(ENV_INTERRUPTIBLE);

    let base = RuntimeConfig {
        trace: true,
        interruptible: false,
        ..RuntimeConfig::default()
    };
    let resolved = RuntimeBuilder::new()
        .config(base.clone())
        .with_env_overrides()
        .start_time(Time::from_millis(7))
        .resolve();
    let ignored = RuntimeBuilder::new().config(base).resolve();
    let bad = {
        std::env::set_var(ENV_TRACE, "sometimes");
        let result = RuntimeBuilder::new().with_env_overrides().resolve();
        std::env::remove_var(ENV_TRACE);
        result
    };
    std::env::remove_var(ENV_TIME_SOURCE);
    std::env::remove_var(ENV_START_TIME_MS);

    let resolved = resolved.expect("valid env");
    assert_with_log!(resolved.time_source == TimeSourceKind::Virtual, "env time source", "virtual", resolved.time_source);
    assert_with_log!(!resolved.trace, "env beats base", false, resolved.trace);
    assert_with_log!(!resolved.interruptible, "unset var keeps base", false, resolved.interruptible);
    assert_with_log!(
        resolved.start_time == Some(Time::from_millis(7)),
        "builder beats env",
        Some(Time::from_millis(7)),
        resolved.start_time
    );

    let ignored = ignored.expect("no env layer");
    assert_with_log!(ignored.time_source == TimeSourceKind::Wall, "env not read by default", "wall", ignored.time_source);

    let category = bad.err().map(|error| error.category());
    assert_with_log!(
        category == Some(ErrorCategory::Configuration),
        "bad value is a config error",
        Some(ErrorCategory::Configuration),
        category
    );
    test_complete!("env_layer_sits_between_base_config_and_builder_methods");
}

#[cfg(feature = "config-file")]
#[test]
fn toml_file_is_the_lowest_explicit_layer() {
    init_test("toml_file_is_the_lowest_explicit_layer");
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("runtime.toml");
    std::fs::write(
        &path,
        "[clock]\ntime_source = \"virtual\"\nstart_time_ms = 900\n\n[fibers]\ninterruptible = false\n",
    )
    .expect("write");

    let runtime = RuntimeBuilder::new()
        .from_toml_file(&path)
        .expect("load")
        .interruptible(true)
        .build()
        .expect("build");
    let config = runtime.config().clone();
    assert_with_log!(config.time_source == TimeSourceKind::Virtual, "file time source", "virtual", config.time_source);
    assert_with_log!(runtime.now() == Time::from_millis(900), "file start time", Time::from_millis(900), runtime.now());
    assert_with_log!(config.interruptible, "builder beats file", true, config.interruptible);

    let unknown = RuntimeBuilder::new().from_toml_str("[engine]\nspeed = 2\n");
    let category = unknown.err().map(|error| error.category());
    assert_with_log!(
        category == Some(ErrorCategory::Configuration),
        "unknown key rejected",
        Some(ErrorCategory::Configuration),
        category
    );
    test_complete!("toml_file_is_the_lowest_explicit_layer");
}
