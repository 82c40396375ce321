fn main() -> Result<(), Box<dyn std::error::Error>> {
    modelchat::cli::main()
}
