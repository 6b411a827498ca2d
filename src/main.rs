fn main() {
    if let Err(err) = sqlmate::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
