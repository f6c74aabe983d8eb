// Peripheral bindings. ESP-IDF drivers on device, simulated stand-ins on any
// hosted target.

#[cfg(target_os = "espidf")]
pub mod adc;
#[cfg(target_os = "espidf")]
pub mod partition;
#[cfg(target_os = "espidf")]
pub mod twdt;

#[cfg(not(target_os = "espidf"))]
pub mod sim;
