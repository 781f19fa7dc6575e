pub mod nmp;
