use crate::command::{is_control_code, is_secure_string_code};

/// Where an inbound envelope is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Client registration bookkeeping
    Control,
    /// Secure-string request or response
    SecureString,
    /// Everything else goes to the application listener
    Listener,
}

/// Picks the route for an inbound command code
pub fn route(command_code: i32) -> Route {
    if is_control_code(command_code) {
        Route::Control
    } else if is_secure_string_code(command_code) {
        Route::SecureString
    } else {
        Route::Listener
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::codes;

    #[test]
    fn codes_are_routed_by_family() {
        assert_eq!(route(codes::REGISTER_CLIENT), Route::Control);
        assert_eq!(route(codes::UNREGISTER_CLIENT), Route::Control);
        assert_eq!(route(codes::SECURE_STRING_REQUEST), Route::SecureString);
        assert_eq!(route(codes::DEVICE_STATUS), Route::Listener);
        assert_eq!(route(codes::REBOOT), Route::Listener);
        assert_eq!(route(4242), Route::Listener);
    }
}
