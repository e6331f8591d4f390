use super::*;

#[test]
fn test_manifest_from_toml() {
    let raw = r#"
        id = "billing"
        name = "Billing"
        version = "2.1.0"
        description = "Invoices and payments"

        [boundary]
        kind = "process"
        command = "./billing-module"
        args = ["--stdio"]

        [config]
        currency = "EUR"
    "#;

    let manifest: ModuleManifest = toml::from_str(raw).unwrap();
    assert_eq!(manifest.id, "billing");
    assert_eq!(manifest.version, Version::new(2, 1, 0));
    assert_eq!(manifest.boundary.kind, "process");
    assert_eq!(manifest.boundary.command.as_deref(), Some("./billing-module"));
    assert_eq!(manifest.boundary.args, vec!["--stdio".to_string()]);
    assert_eq!(manifest.config["currency"], "EUR");
}

#[test]
fn test_manifest_minimal_defaults() {
    let manifest: ModuleManifest = toml::from_str(r#"id = "echo""#).unwrap();
    assert_eq!(manifest.version, Version::default());
    assert_eq!(manifest.boundary.kind, "builtin");
    assert!(manifest.config.is_null());
    assert_eq!(manifest.display_name(), "echo");
}

#[test]
fn test_manifest_builder() {
    let manifest = ModuleManifest::new("diag", "Diagnostics", Version::new(0, 3, 0))
        .with_description("Kernel diagnostics")
        .with_config(serde_json::json!({"verbose": true}));

    assert_eq!(manifest.display_name(), "Diagnostics");
    assert_eq!(manifest.description, "Kernel diagnostics");
    assert_eq!(manifest.config["verbose"], true);
}

#[test]
fn test_module_state_can_load() {
    assert!(ModuleState::Discovered.can_load());
    assert!(ModuleState::Unloaded.can_load());
    assert!(ModuleState::Error.can_load());
    assert!(!ModuleState::Loading.can_load());
    assert!(!ModuleState::Loaded.can_load());
    assert!(!ModuleState::Unloading.can_load());
}

#[test]
fn test_module_state_display() {
    assert_eq!(ModuleState::Unloading.to_string(), "unloading");
}
