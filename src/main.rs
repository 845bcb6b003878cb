fn main() {
    if let Err(e) = ytrssil_lib::run() {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
