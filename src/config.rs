use std::env;

pub struct GatewaySettings {
    pub api_base: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub verify_timeout_secs: u64,
}

pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub gateway: GatewaySettings,
    pub admin_api_token: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let frontend_origin = env::var("FRONTEND_ORIGIN").expect("FRONTEND_ORIGIN must be set");

        let gateway = GatewaySettings {
            api_base: env::var("GATEWAY_API_BASE").expect("GATEWAY_API_BASE must be set"),
            api_key: env::var("GATEWAY_API_KEY").expect("GATEWAY_API_KEY must be set"),
            webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET")
                .expect("GATEWAY_WEBHOOK_SECRET must be set"),
            verify_timeout_secs: env::var("GATEWAY_VERIFY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(10),
        };

        let admin_api_token = env::var("ADMIN_API_TOKEN").expect("ADMIN_API_TOKEN must be set");

        Config {
            database_url,
            frontend_origin,
            gateway,
            admin_api_token,
        }
    }
}
