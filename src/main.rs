use colored::Colorize;

fn main() {
    if let Err(e) = seqlaunch::run() {
        // already logged, unless logging is off:
        if !log::log_enabled!(log::Level::Error) {
            eprintln!("{} {e:#}", "FATAL".red());
        }
        std::process::exit(1);
    }
}
