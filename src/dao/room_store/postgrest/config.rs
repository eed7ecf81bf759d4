/// Runtime configuration describing how to reach a PostgREST endpoint and its realtime socket.
#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    /// REST root, e.g. `https://project.supabase.co/rest/v1`.
    pub base_url: String,
    /// Realtime websocket endpoint, e.g. `wss://project.supabase.co/realtime/v1/websocket`.
    pub realtime_url: String,
    /// Key sent as `apikey` header and bearer token.
    pub api_key: String,
    /// Database schema exposed by the endpoint.
    pub schema: String,
}

impl PostgrestConfig {
    /// Construct a configuration from explicit endpoints and key.
    pub fn new(
        base_url: impl Into<String>,
        realtime_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            realtime_url: realtime_url.into(),
            api_key: api_key.into(),
            schema: "public".into(),
        }
    }

    /// Use a schema other than `public`.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }
}
