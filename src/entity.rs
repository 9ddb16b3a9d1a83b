//! `entity!`: the explicit class descriptor DSL called for by `spec.md`
//! §9's first design note ("Dynamic class configuration → explicit class
//! descriptors ... consumed by a constructor-factory that produces typed
//! item instances").
//!
//! One invocation declares an entity's table, key, fields, and indexes,
//! and expands to:
//! - a zero-sized marker type implementing [`crate::model::Entity`],
//! - a `'static` [`crate::model::EntityDescriptor`] built once behind a
//!   `OnceLock` and validated on first access (`spec.md` §4.3 "class
//!   preparation"),
//! - typed `get_*`/`set_*`/(`increment_*` for fields marked `numeric`)
//!   accessor methods on `Model<Marker>`.

/// Declares an entity. See the module docs for the generated surface.
///
/// A field (or a sort-key component — the sole key role allowed one) may
/// carry a trailing `= <expr>` default, applied at CREATE/CREATE_OR_PUT time
/// whenever the caller omits that field (`spec.md` §4.3).
///
/// ```ignore
/// entity! {
///     name: Order,
///     table: "orders",
///     partition: [ id: String [] ],
///     sort: [],
///     fields: [
///         product: String [],
///         quantity: i64 [numeric],
///         status: String [] = "pending".to_owned(),
///     ],
///     indexes: [],
/// }
/// ```
#[macro_export]
macro_rules! entity {
    (
        name: $name:ident,
        table: $table:literal,
        partition: [ $( $pk_name:ident : $pk_ty:ty [ $($pk_attr:ident),* ] $(= $pk_default:expr)? ),* $(,)? ],
        sort: [ $( $sk_name:ident : $sk_ty:ty [ $($sk_attr:ident),* ] $(= $sk_default:expr)? ),* $(,)? ],
        fields: [ $( $f_name:ident : $f_ty:ty [ $($f_attr:ident),* ] $(= $f_default:expr)? ),* $(,)? ],
        indexes: [ $( $idx:expr ),* $(,)? ] $(,)?
    ) => {
        #[derive(Clone, Copy, Debug)]
        pub struct $name;

        impl $crate::model::Entity for $name {
            const TABLE: &'static str = $table;

            fn descriptor() -> &'static $crate::model::EntityDescriptor {
                static DESCRIPTOR: ::std::sync::OnceLock<$crate::model::EntityDescriptor> =
                    ::std::sync::OnceLock::new();
                DESCRIPTOR.get_or_init(|| {
                    static FIELDS: &[$crate::model::FieldDescriptor] = &[
                        $(
                            $crate::entity!(@field $pk_name, $pk_ty, $crate::field::KeyRole::Partition, [ $($pk_attr),* ], [ $($pk_default)? ]),
                        )*
                        $(
                            $crate::entity!(@field $sk_name, $sk_ty, $crate::field::KeyRole::Sort, [ $($sk_attr),* ], [ $($sk_default)? ]),
                        )*
                        $(
                            $crate::entity!(@field $f_name, $f_ty, $crate::field::KeyRole::None, [ $($f_attr),* ], [ $($f_default)? ]),
                        )*
                    ];
                    static INDEXES: &[$crate::model::IndexDef] = &[ $( $idx ),* ];
                    let descriptor = $crate::model::EntityDescriptor {
                        name: stringify!($name),
                        fields: FIELDS,
                        indexes: INDEXES,
                        ttl_field: $crate::entity!(@ttl_field [ $($f_name [ $($f_attr),* ]),* ]),
                    };
                    descriptor
                        .validate()
                        .unwrap_or_else(|e| panic!("invalid entity descriptor for `{}`: {e}", stringify!($name)));
                    descriptor
                })
            }
        }

        impl $crate::item::Model<$name> {
            $(
                $crate::entity!(@accessors $pk_name, $pk_ty, [ $($pk_attr),* ]);
            )*
            $(
                $crate::entity!(@accessors $sk_name, $sk_ty, [ $($sk_attr),* ]);
            )*
            $(
                $crate::entity!(@accessors $f_name, $f_ty, [ $($f_attr),* ]);
            )*
        }
    };

    (@field $name:ident, $ty:ty, $role:expr, [ $($attr:ident),* ], [ $($default:expr)? ]) => {
        $crate::model::FieldDescriptor {
            name: stringify!($name),
            key_role: $role,
            kind: if $crate::entity!(@has_attr numeric [ $($attr),* ]) {
                $crate::model::FieldKind::Number
            } else {
                $crate::model::FieldKind::String
            },
            optional: $crate::entity!(@has_attr optional [ $($attr),* ]),
            immutable: match $role {
                $crate::field::KeyRole::None => $crate::entity!(@has_attr immutable [ $($attr),* ]),
                _ => true,
            },
            default: $crate::entity!(@default_fn $ty, [ $($default)? ]),
        }
    };

    (@default_fn $ty:ty, [ ]) => { ::std::option::Option::None };
    (@default_fn $ty:ty, [ $default:expr ]) => {
        ::std::option::Option::Some((|| -> $crate::value::Value {
            let value: $ty = $default;
            $crate::field::FieldType::to_value(&value)
        }) as fn() -> $crate::value::Value)
    };

    (@has_attr $needle:ident [ ]) => { false };
    (@has_attr $needle:ident [ $head:ident $(, $tail:ident)* ]) => {
        $crate::entity!(@attr_eq $needle $head) || $crate::entity!(@has_attr $needle [ $($tail),* ])
    };
    (@attr_eq optional optional) => { true };
    (@attr_eq immutable immutable) => { true };
    (@attr_eq numeric numeric) => { true };
    (@attr_eq $a:ident $b:ident) => { false };

    (@ttl_field [ ]) => { ::std::option::Option::None };
    (@ttl_field [ $name:ident [ $($attr:ident),* ] $(, $tail_name:ident [ $($tail_attr:ident),* ])* ]) => {
        if $crate::entity!(@has_attr ttl [ $($attr),* ]) {
            ::std::option::Option::Some(stringify!($name))
        } else {
            $crate::entity!(@ttl_field [ $($tail_name [ $($tail_attr),* ]),* ])
        }
    };

    (@accessors $name:ident, $ty:ty, [ $($attr:ident),* ]) => {
        $crate::entity!(@paste_get $name, $ty);
        $crate::entity!(@paste_set $name, $ty, [ $($attr),* ]);
        $crate::entity!(@paste_incr $name, $ty, [ $($attr),* ]);
    };

    (@paste_get $name:ident, $ty:ty) => {
        ::paste::paste! {
            #[doc = concat!("Marks `", stringify!($name), "` read and returns its current value.")]
            pub fn [<$name>](&mut self) -> $crate::error::Result<::std::option::Option<$ty>> {
                self.get_typed(stringify!($name))
            }
        }
    };

    (@paste_set $name:ident, $ty:ty, [ $($attr:ident),* ]) => {
        $crate::entity!(@paste_set_inner $name, $ty, $crate::entity!(@has_attr immutable [ $($attr),* ]));
    };
    (@paste_set_inner $name:ident, $ty:ty, false) => {
        ::paste::paste! {
            #[doc = concat!("Sets `", stringify!($name), "`.")]
            pub fn [<set_ $name>](&mut self, value: $ty) -> $crate::error::Result<()> {
                self.set_typed(stringify!($name), value)
            }
        }
    };
    (@paste_set_inner $name:ident, $ty:ty, true) => {};

    (@paste_incr $name:ident, $ty:ty, [ $($attr:ident),* ]) => {
        $crate::entity!(@paste_incr_inner $name, $ty, $crate::entity!(@has_attr numeric [ $($attr),* ]));
    };
    (@paste_incr_inner $name:ident, $ty:ty, true) => {
        ::paste::paste! {
            #[doc = concat!("Increments `", stringify!($name), "` by `delta`.")]
            pub fn [<increment_ $name>](&mut self, delta: impl ::std::convert::Into<::rust_decimal::Decimal>) -> $crate::error::Result<()> {
                self.increment_typed(stringify!($name), delta.into())
            }
        }
    };
    (@paste_incr_inner $name:ident, $ty:ty, false) => {};
}
