//! The object model: NaN-boxed values, heap object headers, and the
//! table object that backs named and indexed property storage.

pub mod header;
pub mod heap;
pub mod table;
pub mod value;

pub use header::{Header, HeaderFlags, ObjectType};
pub use heap::{Heap, StringObject};
pub use table::{GetByIdIcInfo, GetByIntegerIcInfo, PutByIdIcInfo, TableObject};
pub use value::TValue;

/// Read the object type of a heap value through its header.
///
/// # Safety
///
/// `value` must be a pointer to a live heap object whose first word is a
/// [`Header`].
#[inline(always)]
pub unsafe fn object_type_of(value: TValue) -> ObjectType {
    unsafe { value.as_obj::<Header>().object_type() }
}
