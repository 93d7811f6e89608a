use core::ops;

/// Memory for a fixed number of objects, handed in by the caller.
///
/// The length never changes after construction. Tables of the stack are sized by the slice they
/// are given and report running out of entries instead of growing.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Slice<'a, T: 'a> {
    /// Objects in an owned vector, for hosted programs and tests.
    #[cfg(feature = "std")]
    Many(Vec<T>),

    /// Objects living in borrowed memory, e.g. a `static` array.
    Borrowed(&'a mut [T]),
}

impl<'a, T: 'a> Slice<'a, T> {
    /// View the objects.
    pub fn as_slice(&self) -> &[T] {
        match self {
            #[cfg(feature = "std")]
            Slice::Many(vec) => vec.as_slice(),
            Slice::Borrowed(slice) => slice,
        }
    }

    /// Mutably view the objects.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match self {
            #[cfg(feature = "std")]
            Slice::Many(vec) => vec.as_mut_slice(),
            Slice::Borrowed(slice) => slice,
        }
    }
}

/// No memory at all.
impl<T> Default for Slice<'_, T> {
    fn default() -> Self {
        Slice::Borrowed(<&mut [T]>::default())
    }
}

#[cfg(feature = "std")]
impl<T> From<Vec<T>> for Slice<'_, T> {
    fn from(vec: Vec<T>) -> Self {
        Slice::Many(vec)
    }
}

impl<'a, T> From<&'a mut [T]> for Slice<'a, T> {
    fn from(slice: &'a mut [T]) -> Self {
        Slice::Borrowed(slice)
    }
}

impl<T> ops::Deref for Slice<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T> ops::DerefMut for Slice<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}
