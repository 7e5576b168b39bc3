use std::process::ExitCode;

fn main() -> ExitCode {
    lapsel_cli::run()
}
