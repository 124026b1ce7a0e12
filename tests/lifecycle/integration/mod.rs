mod test_backup;
mod test_bootstrap;
mod test_monitoring;
mod test_rotation;
mod test_store;
