use pg_reservation_pool::api::pool_dto::RunDto;
use pg_reservation_pool::domain::reservation_pool::executor::trial::TrialStatus;
use pg_reservation_pool::error::Error;
use pg_reservation_pool::loader::parser::{parse_json_file, parse_json_str};
use pg_reservation_pool::{build_runner, run_from_file};

fn scenario_path() -> String {
    format!("{}/configs/scenario_a.json", env!("CARGO_MANIFEST_DIR"))
}

fn run_dto(pool: &str, nodes: &str, bundles: &str) -> RunDto {
    let json = format!(r#"{{ "pool": {}, "cluster": {{ "nodes": {} }}, "trials": [ {{ "count": 2, "resources": {{ "bundles": {} }}, "durationTicks": 1 }} ] }}"#, pool, nodes, bundles);
    parse_json_str(&json).unwrap()
}

#[test]
fn scenario_file_is_parsed() {
    let dto: RunDto = parse_json_file(scenario_path()).unwrap();

    assert_eq!(dto.pool.max_pending_reservations, Some(4));
    assert!(dto.pool.reuse_enabled);
    assert_eq!(dto.cluster.nodes.len(), 1);
    assert_eq!(dto.cluster.ready_after_polls, 1);
    assert_eq!(dto.trials[0].count, 10);
    assert!(dto.clock.is_simulation);
    assert_eq!(dto.max_ticks, Some(200));
}

#[test]
fn scenario_file_runs_to_completion() {
    let report = run_from_file(scenario_path(), None).unwrap();

    assert_eq!(report.count(TrialStatus::Terminated), 10);
    assert_eq!(report.max_in_use(), 2);
    assert!(report.drained);
    assert_eq!(report.backend_live_after_shutdown, 0);
}

#[test]
fn defaults_fill_missing_options() {
    let dto = run_dto("{}", r#"[{ "id": "n1", "resources": { "CPU": 1 } }]"#, r#"[{ "CPU": 1 }]"#);
    assert!(dto.max_ticks.is_none());
    assert!(!dto.clock.is_simulation);

    let runner = build_runner(dto).unwrap();
    let config = runner.pool().config();
    assert_eq!(config.max_pending_reservations, None);
    assert!(!config.reuse_enabled);
    assert_eq!(config.cache_capacity_per_spec, 1);
    assert_eq!(config.max_creation_retries, 3);
    assert_eq!(runner.trials().len(), 2);
}

#[test]
fn invalid_descriptions_are_rejected() {
    let node = r#"[{ "id": "n1", "resources": { "CPU": 1 } }]"#;
    let bundle = r#"[{ "CPU": 1 }]"#;

    let zero_limit = build_runner(run_dto(r#"{ "maxPendingReservations": 0 }"#, node, bundle));
    assert!(matches!(zero_limit, Err(Error::ConfigError(_))));

    let no_nodes = build_runner(run_dto("{}", "[]", bundle));
    assert!(matches!(no_nodes, Err(Error::ConfigError(_))));

    let negative_capacity = build_runner(run_dto("{}", r#"[{ "id": "n1", "resources": { "CPU": -1 } }]"#, bundle));
    assert!(matches!(negative_capacity, Err(Error::ConfigError(_))));

    let empty_bundle = build_runner(run_dto("{}", node, "[{}]"));
    assert!(matches!(empty_bundle, Err(Error::SpecInvalid(_))));

    let negative_bundle = build_runner(run_dto("{}", node, r#"[{ "CPU": -2 }]"#));
    assert!(matches!(negative_bundle, Err(Error::SpecInvalid(_))));
}

#[test]
fn unreadable_files_surface_loader_errors() {
    assert!(matches!(run_from_file("does/not/exist.json", None), Err(Error::IoError(_))));
    assert!(matches!(parse_json_str::<RunDto>("{ \"pool\": "), Err(Error::DeserializationError(_))));
}
