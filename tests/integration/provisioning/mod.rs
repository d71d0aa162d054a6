mod converge_test;
mod refresh_test;
mod resume_test;
mod test_utils;
