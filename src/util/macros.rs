/// Report an unrecoverable invariant violation and abort.
///
/// The region core never returns errors: it either completes an operation or
/// terminates the program (see the crate-level error handling notes). The
/// message goes through the `log` facade before the panic so it reaches
/// whatever sink the embedder configured.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        log::error!("{}", message);
        panic!("{}", message);
    }};
}
