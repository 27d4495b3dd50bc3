fn main() {
    // Only the firmware build links against ESP-IDF.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        // Propagate ESP-IDF link/cfg/include args from esp-idf-sys.
        if let Err(err) = embuild::build::LinkArgs::output_propagated("ESP_IDF") {
            println!("cargo:warning=esp-idf link args not propagated: {err}");
        }
        if let Err(err) = embuild::build::CfgArgs::output_propagated("ESP_IDF") {
            println!("cargo:warning=esp-idf cfg args not propagated: {err}");
        }
    }

    println!("cargo:rerun-if-env-changed=DHT11_GPIO");
    println!("cargo:rerun-if-env-changed=DHT11_SAMPLE_PERIOD_MS");
    println!("cargo:rerun-if-env-changed=DHT11_HANDOFF_TIMEOUT_MS");
    println!("cargo:rerun-if-env-changed=DHT11_OFFLINE_AFTER");
}
