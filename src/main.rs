fn main() -> Result<(), demo_core::DemoError> {
    env_logger::init();
    demo_core::run(&demo_core::DemoConfig::from_env())
}
