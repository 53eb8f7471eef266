//! Integration tests: the sensor manager, simulation and service run against
//! an in-memory BLE backend.
