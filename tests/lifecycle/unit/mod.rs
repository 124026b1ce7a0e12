mod test_config;
mod test_issuance;
mod test_properties;
mod test_validation;
