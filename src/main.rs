use polyhls::driver;
use std::panic;
use std::process::ExitCode;

fn main() -> ExitCode {
    match panic::catch_unwind(driver::run_compiler) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(errs)) => {
            for e in errs.errors() {
                eprintln!("Error: {e}");
            }
            ExitCode::from(1)
        }
        // The panic hook has already printed the message.
        Err(_) => ExitCode::from(2),
    }
}
