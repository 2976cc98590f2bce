pub mod balance_writer;
