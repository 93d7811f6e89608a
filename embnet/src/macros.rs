/// An enum over a raw integer field where only some values are named.
///
/// Header fields such as the EtherType or the ICMP type are registries: the stack names the values
/// it acts on and must still carry every other value through unchanged. The generated enum has an
/// extra `Unknown` variant for those, and converts from and into the raw integer.
///
/// # Example
///
/// ```ignore
/// enum_with_unknown! {
///     /// The hardware address space of an ARP packet.
///     pub enum Hardware(u16) {
///         Ethernet = 1,
///     }
/// }
///
/// assert_eq!(Hardware::from(1), Hardware::Ethernet);
/// assert_eq!(Hardware::from(6), Hardware::Unknown(6));
/// ```
// Copyright (C) 2016 whitequark@whitequark.org
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $( $variant:ident = $value:expr ),+ $(,)*
        }
    ) => {
        enum_with_unknown! {
            $( #[$enum_attr] )*
            pub doc enum $name($ty) {
                $( #[doc = stringify!($variant)] $variant = $value ),+
            }
        }
    };
    (
        $( #[$enum_attr:meta] )*
        pub doc enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )+
              $variant:ident = $value:expr $(,)*
            ),+
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Any value without a name above.
            Unknown($ty)
        }

        impl $name {
            /// Whether the value is none of the named variants.
            pub fn is_unknown(self) -> bool {
                match self {
                    $name::Unknown(_) => true,
                    _ => false,
                }
            }
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// An unsized newtype over `[u8]` for header views.
///
/// The wrapped type gets two private constructors, `__from_macro_new_unchecked` and
/// `__from_macro_new_unchecked_mut`, which reinterpret a (mutable) byte slice without any checks.
/// The public constructors of a header are built on them and validate lengths as needed.
///
/// ```
/// # use embnet::byte_wrapper;
/// byte_wrapper! {
///     /// The first fourteen bytes of a frame.
///     pub struct frame_header([u8]);
/// }
///
/// impl frame_header {
///     pub fn from_slice(slice: &[u8]) -> &Self {
///         Self::__from_macro_new_unchecked(slice)
///     }
/// }
///
/// let data = [0xff; 14];
/// let _ = frame_header::from_slice(&data);
/// ```
#[macro_export]
macro_rules! byte_wrapper {
    (
        $( #[$attr:meta] )*
        pub struct $name:ident([u8])$(;)*
    ) => {
        #[allow(non_camel_case_types)]
        #[repr(transparent)]
        $( #[$attr] )*
        pub struct $name([u8]);

        impl $name {
            #[allow(dead_code)]
            fn __from_macro_new_unchecked(data: &[u8]) -> &Self {
                // SAFETY: `Self` is a transparent wrapper of `[u8]`.
                unsafe { &*(data as *const [u8] as *const Self) }
            }

            #[allow(dead_code)]
            fn __from_macro_new_unchecked_mut(data: &mut [u8]) -> &mut Self {
                // SAFETY: `Self` is a transparent wrapper of `[u8]`.
                unsafe { &mut *(data as *mut [u8] as *mut Self) }
            }
        }
    }
}

#[cfg(feature = "log")]
#[macro_use]
mod logging {
    macro_rules! net_log {
        (trace, $($arg:expr),*) => { ::log::trace!($($arg),*) };
        (debug, $($arg:expr),*) => { ::log::debug!($($arg),*) };
    }
}

#[cfg(not(feature = "log"))]
#[macro_use]
mod logging {
    macro_rules! net_log {
        ($level:ident, $($arg:expr),*) => { { $( let _ = &$arg; )* } }
    }
}

macro_rules! net_trace {
    ($($arg:expr),*) => (net_log!(trace, $($arg),*));
}

macro_rules! net_debug {
    ($($arg:expr),*) => (net_log!(debug, $($arg),*));
}
