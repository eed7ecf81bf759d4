/// Who is acting. Passed explicitly to every operation that depends on the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Opaque token issued by the identity provider.
    pub user_token: String,
    /// Name shown to other participants.
    pub display_name: String,
}

impl SessionContext {
    /// Session for `user_token` shown as `display_name`.
    pub fn new(user_token: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_token: user_token.into(),
            display_name: display_name.into(),
        }
    }
}
