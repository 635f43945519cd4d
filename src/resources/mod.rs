pub mod kueues;
