fn main() -> std::process::ExitCode {
    custody_etl_lib::run()
}
