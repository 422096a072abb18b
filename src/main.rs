use std::process;

fn main() {
    if let Err(err) = rhake::run() {
        rhake::printer::error(format!("rhake: {}", err));
        process::exit(err.exit_code());
    }
}
