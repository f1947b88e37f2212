fn main() {
    if let Err(err) = bucket_matrix::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
