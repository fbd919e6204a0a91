use std::panic;

pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        log::error!("{}", panic_message(panic_info));
        log::logger().flush();

        default_hook(panic_info);

        std::process::exit(1);
    }));
}

/// One-line description of a panic for the log file.
pub fn panic_message(info: &panic::PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>");
    match info.location() {
        Some(location) => format!(
            "panic at {}:{}: {message}",
            location.file(),
            location.line()
        ),
        None => format!("panic: {message}"),
    }
}
