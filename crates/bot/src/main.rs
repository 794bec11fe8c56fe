use std::process::ExitCode;

fn main() -> ExitCode {
    musicof_bot::run()
}
