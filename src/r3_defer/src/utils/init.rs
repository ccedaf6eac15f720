/// A constant default value. Objects of this crate are usually placed in
/// `static`s, where `Default::default` can't be used.
pub trait Init {
    const INIT: Self;
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

impl Init for u8 {
    const INIT: Self = 0;
}

impl Init for u32 {
    const INIT: Self = 0;
}
