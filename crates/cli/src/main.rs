use std::process::ExitCode;

fn main() -> ExitCode {
    resq_cli::run()
}
