fn main() -> anyhow::Result<()> {
    provision_wizard::cli::main()
}
