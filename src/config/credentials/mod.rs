use super::schema::Config;

macro_rules! define_credentials {
    ($( $env:literal => $($path:ident).+ );* $(;)?) => {
        /// Environment variables that override secrets from `config.json`.
        pub const CREDENTIAL_ENV_VARS: &[&str] = &[$($env),*];

        /// Apply environment variable overrides.
        ///
        /// Any `PARLEY_*` variable that is set and non-empty overwrites the
        /// corresponding config field, so secrets can be injected without
        /// touching the config file.
        pub fn apply_env_overrides(config: &mut Config) {
            $(
                if let Ok(val) = std::env::var($env) {
                    if !val.is_empty() {
                        config.$($path).+ = val;
                    }
                }
            )*
        }
    };
}

define_credentials! {
    "PARLEY_TELEGRAM_TOKEN"     => telegram.token;
    "PARLEY_OPENAI_API_KEY"     => providers.openai.api_key;
    "PARLEY_ANTHROPIC_API_KEY"  => providers.anthropic.api_key;
}
