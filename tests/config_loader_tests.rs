use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;
use upload_api::config::{ConfigError, ConfigLoader};

const KEYS: &[&str] = &[
    "UPLOAD_PROFILE",
    "UPLOAD_API_BIND_ADDR",
    "UPLOAD_LOG_LEVEL",
    "UPLOAD_PROJECT_ID",
    "UPLOAD_DATASET_ID",
    "UPLOAD_API_KEY",
    "UPLOAD_API_KEY_SECRET",
    "UPLOAD_LOAD_JOB_POLL_INTERVAL_MS",
    "UPLOAD_CORS_ALLOWED_ORIGINS",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for key in KEYS {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn base_env(dir: &TempDir) {
    write_env_file(
        dir,
        ".env",
        "UPLOAD_PROJECT_ID=acme-analytics\nUPLOAD_DATASET_ID=hr\n",
    );
}

#[test]
fn loads_defaults_with_required_ids() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    base_env(&temp_dir);

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.project_id, "acme-analytics");
    assert_eq!(cfg.dataset_id, "hr");
    assert_eq!(cfg.load_job_poll_interval_ms, 1000);
    assert_eq!(cfg.cors_allowed_origins, vec!["*".to_string()]);
    assert_eq!(cfg.bigquery_api_base, "https://bigquery.googleapis.com");
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn missing_project_id_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("project id is required");
    assert!(matches!(err, ConfigError::MissingProjectId));
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "UPLOAD_PROJECT_ID=acme-analytics\nUPLOAD_DATASET_ID=hr\nUPLOAD_API_BIND_ADDR=127.0.0.1:3000\n",
    );
    write_env_file(&temp_dir, ".env.test", "UPLOAD_API_BIND_ADDR=192.168.0.10:5000\n");
    write_env_file(&temp_dir, ".env.test.local", "UPLOAD_API_BIND_ADDR=10.0.0.5:6000\n");

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "UPLOAD_PROFILE=test\nUPLOAD_API_BIND_ADDR=127.0.0.1:4000\nUPLOAD_API_KEY=local-key\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.api_key.as_deref(), Some("local-key"));
    clear_env();
}

#[test]
fn unprefixed_keys_are_ignored() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "UPLOAD_PROJECT_ID=acme-analytics\nUPLOAD_DATASET_ID=hr\nDATASET_ID=other\nAPI_BIND_ADDR=1.2.3.4:1\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().unwrap();
    assert_eq!(cfg.dataset_id, "hr");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "UPLOAD_PROJECT_ID=acme-analytics\nUPLOAD_DATASET_ID=hr\nUPLOAD_API_BIND_ADDR=127.0.0.1:3000\n",
    );

    unsafe {
        env::set_var("UPLOAD_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("UPLOAD_CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(
        cfg.cors_allowed_origins,
        vec!["https://a.example".to_string(), "https://b.example".to_string()]
    );

    clear_env();
}

#[test]
fn production_without_key_source_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    base_env(&temp_dir);
    unsafe {
        env::set_var("UPLOAD_PROFILE", "production");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("key source required outside local/test");
    assert!(matches!(err, ConfigError::MissingApiKeySource));

    unsafe {
        env::set_var("UPLOAD_API_KEY_SECRET", "upload-api-key");
    }
    assert!(loader.load().is_ok());

    clear_env();
}

#[test]
fn invalid_numbers_and_addresses_return_errors() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    base_env(&temp_dir);
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));

    unsafe {
        env::set_var("UPLOAD_LOAD_JOB_POLL_INTERVAL_MS", "soon");
    }
    let err = loader.load().expect_err("non-numeric interval should fail");
    assert!(matches!(err, ConfigError::InvalidNumber { .. }));

    unsafe {
        env::remove_var("UPLOAD_LOAD_JOB_POLL_INTERVAL_MS");
        env::set_var("UPLOAD_API_BIND_ADDR", "not-an-addr");
    }
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));

    clear_env();
}
