fn main() -> anyhow::Result<()> {
    keycount::run()
}
