mod picture_fetcher_port;

pub use picture_fetcher_port::PictureFetcherPort;
