use barge_broker::BrokerConfig;

/// Filemanager configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct FileManagerConfig {
    /// Base directory for bucket storage (`FILE_FOLDER`).
    pub storage_path: String,
    pub broker: BrokerConfig,
}

impl FileManagerConfig {
    pub fn from_env() -> Self {
        let connection_name = format!("filemanager@{}", host());
        Self {
            storage_path: std::env::var("FILE_FOLDER")
                .unwrap_or_else(|_| "/tmp/fileDump".to_string()),
            broker: BrokerConfig::from_env().with_connection_name(connection_name),
        }
    }
}

fn host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into())
}
