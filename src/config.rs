use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    pub base_url: String,
    pub api_key: Option<String>,
    pub session: String,
    pub data_dir: PathBuf,
    pub qr_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let debug = cfg!(debug_assertions);
        let base_url = env::var("CHATBRIDGE_API_BASE_URL").unwrap_or_else(|_| {
            if debug {
                "http://localhost:3000".to_string()
            } else {
                "http://waha:3000".to_string()
            }
        });
        let base_url = base_url.trim_end_matches('/').to_string();

        let api_key = env::var("CHATBRIDGE_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let session = env::var("CHATBRIDGE_SESSION")
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "default".to_string());

        let data_dir = env::var("CHATBRIDGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir(debug));
        let qr_path = env::var("CHATBRIDGE_QR_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("login-qr.png"));

        Self {
            base_url,
            api_key,
            session,
            data_dir,
            qr_path,
        }
    }
}

fn default_data_dir(debug: bool) -> PathBuf {
    let base = env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    let dir_name = if debug { "chatbridge-dev" } else { "chatbridge" };
    base.join(".local").join("share").join(dir_name)
}
