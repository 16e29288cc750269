mod helpers;
mod tests_basic;
mod tests_corruption;
mod tests_scan;
