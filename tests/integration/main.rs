mod provisioning;

#[cfg(feature = "integration-tests")]
mod aws;
