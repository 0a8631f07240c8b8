fn main() {
    if let Err(error) = studyclock::run() {
        eprintln!("studyclock: {error}");
        std::process::exit(1);
    }
}
