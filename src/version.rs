/// Reported by `--version` and in the dashboard user agent. Release builds
/// may stamp their own value through `APP_VERSION`.
pub const VERSION: &str = match option_env!("APP_VERSION") {
    Some(stamped) => stamped,
    None => env!("CARGO_PKG_VERSION"),
};
