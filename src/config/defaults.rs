//! Built-in defaults
//!
//! Values for the one board this lane serves: the Axiometa PIXIE M1
//! (ESP32-S3, 4MB flash, native USB CDC).

/// Default build root, relative to the working directory.
pub const BUILD_ROOT: &str = "builds";

/// Compiler CLI.
pub const TOOLCHAIN_CLI: &str = "arduino-cli";

/// Board platform that must be installed.
pub const PLATFORM: &str = "esp32:esp32";

/// Fully qualified board name, with USB CDC enabled on boot.
pub const FQBN: &str = "esp32:esp32:axiometa_pixie_m1:CDCOnBoot=cdc";

/// Board-manager index that provides the esp32 platform.
pub const ESP32_INDEX_URL: &str =
    "https://espressif.github.io/arduino-esp32/package_esp32_index.json";

/// Flasher launcher and its leading arguments.
pub const FLASHER_PROGRAM: &str = "python";
pub const FLASHER_PROGRAM_ARGS: &[&str] = &["-m", "esptool"];

pub const CHIP: &str = "esp32s3";
pub const BAUD: u32 = 921_600;
pub const BEFORE: &str = "default_reset";
pub const AFTER: &str = "hard_reset";
pub const FLASH_MODE: &str = "dio";
pub const FLASH_FREQ: &str = "80m";
pub const FLASH_SIZE: &str = "4MB";
