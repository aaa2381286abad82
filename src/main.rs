fn main() -> anyhow::Result<()> {
    pocketguard_lib::run()
}
