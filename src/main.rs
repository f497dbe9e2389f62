//! whawty-authd - credential store and authentication agent.
//!
//! This binary is the admin CLI described in the crate docs: it loads a
//! directory configuration, performs one operation, and exits. It does not
//! itself bind the saslauthd listener; that is `sasl::listen_and_serve`,
//! exposed for an external daemon entry point to call.

use std::process::ExitCode;

use whawty_authd::cli::App;

#[tokio::main]
async fn main() -> ExitCode {
    let app = App::init();
    match app.execute().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            exit_code(e.exit_code())
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
