/// Calculate the SHA-1 hash of one or more byte slices concatenated.
#[macro_export]
macro_rules! sha1 {
    ( $( $x:expr ),+ ) => {{
        use sha1::{Digest, Sha1};
        let mut h = Sha1::new();
        $( h.update($x); )+
        let out: [u8; 20] = h.finalize().into();
        out
    }};
}

/// Calculate `HMAC-SHA1(key, data)` for one or more data slices concatenated.
#[macro_export]
macro_rules! hmac_sha1 {
    ( $key:expr, $( $x:expr ),+ ) => {{
        use hmac::{Hmac, Mac};
        use sha1::Sha1;
        let mut h: Hmac<Sha1> = Mac::new_from_slice($key).expect("HMAC accepts any key length");
        $( h.update($x); )+
        let out: [u8; 20] = h.finalize().into_bytes().into();
        out
    }};
}
