//! Element types storable in device memory.
//!
//! The mapping from host element type to device channel format is closed and
//! resolved at compile time: the seven base scalar types, each as a single
//! channel or as a 2- or 4-channel vector. Anything else fails to compile
//! because [`Elem`] is sealed.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    SignedInt8,
    SignedInt16,
    SignedInt32,
    UnsignedInt8,
    UnsignedInt16,
    UnsignedInt32,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    R,
    Rg,
    Rgba,
}

/// Device-side channel layout of an image element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub channel_type: ChannelType,
    pub order: ChannelOrder,
}

mod sealed {
    pub trait Sealed {}
}

/// A type storable in device memory objects.
pub trait Elem: sealed::Sealed + Copy + Send + Sync + 'static {
    const FORMAT: ImageFormat;
}

/// A base scalar type passable to kernels by value.
pub trait Scalar: Elem {}

macro_rules! impl_elem {
    ($t:ty, $ct:ident) => {
        impl sealed::Sealed for $t {}
        impl Elem for $t {
            const FORMAT: ImageFormat = ImageFormat {
                channel_type: ChannelType::$ct,
                order: ChannelOrder::R,
            };
        }
        impl Scalar for $t {}

        impl sealed::Sealed for [$t; 2] {}
        impl Elem for [$t; 2] {
            const FORMAT: ImageFormat = ImageFormat {
                channel_type: ChannelType::$ct,
                order: ChannelOrder::Rg,
            };
        }

        impl sealed::Sealed for [$t; 4] {}
        impl Elem for [$t; 4] {
            const FORMAT: ImageFormat = ImageFormat {
                channel_type: ChannelType::$ct,
                order: ChannelOrder::Rgba,
            };
        }
    };
}

impl_elem!(i8, SignedInt8);
impl_elem!(i16, SignedInt16);
impl_elem!(i32, SignedInt32);
impl_elem!(u8, UnsignedInt8);
impl_elem!(u16, UnsignedInt16);
impl_elem!(u32, UnsignedInt32);
impl_elem!(f32, Float);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_follow_channel_count() {
        assert_eq!(<f32 as Elem>::FORMAT.order, ChannelOrder::R);
        assert_eq!(<[f32; 2] as Elem>::FORMAT.order, ChannelOrder::Rg);
        assert_eq!(<[u8; 4] as Elem>::FORMAT.channel_type, ChannelType::UnsignedInt8);
        assert_eq!(<[u8; 4] as Elem>::FORMAT.order, ChannelOrder::Rgba);
    }
}
