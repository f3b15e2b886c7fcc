mod element_tests;
mod gc_tests;
mod lang_tests;
