fn main() {
    // Only the ESP-IDF build has a sysenv to forward; hosted builds are plain std.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
