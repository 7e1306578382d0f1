//! Quiet-mode aware logging. With SKILLKIT_QUIET=1 lifecycle [INFO] lines are suppressed.

#[macro_export]
macro_rules! info_log {
    ($($arg:tt)*) => {{
        if !$crate::log::is_quiet() {
            tracing::info!($($arg)*);
        }
    }};
}

pub fn is_quiet() -> bool {
    skillkit_core::config::ObservabilityConfig::from_env().quiet
}
