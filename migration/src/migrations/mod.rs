pub mod m202603150001_create_projects;
pub mod m202603150002_create_sweep_sessions;
pub mod m202603150003_create_measurement_points;
pub mod m202603150004_create_waveform_store;
