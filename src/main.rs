fn main() {
    if let Err(e) = contract_intake_lib::run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
