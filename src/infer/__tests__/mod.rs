mod backend_test;
mod session_test;
