mod live_test;
