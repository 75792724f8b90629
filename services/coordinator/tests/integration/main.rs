mod helpers;

mod archiver_test;
mod assignment_test;
mod relay_test;
mod tx_test;
