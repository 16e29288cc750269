mod helpers;
mod tests_basic;
mod tests_flush;
