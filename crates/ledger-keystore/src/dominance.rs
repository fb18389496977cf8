use ledger_core::Role;

/// Whether `caller` may grant or revoke `target`. This is an explicit table,
/// not a derived `Ord` comparison: `Role` orders loosely for display, but
/// dominance is not a total order once `USER` is allowed to mint operational
/// keys that `ADMIN` never touches directly.
pub fn dominates(caller: Role, target: Role) -> bool {
    use Role::*;
    match caller {
        SuperAdmin => matches!(target, SuperAdmin | Admin | User | ReadOnly),
        Admin => matches!(target, User | ReadOnly),
        User => false, // USER never dominates a flat Role; see `dominates_depth` for hierarchical keys.
        ReadOnly => false,
        BootstrapAdmin => matches!(target, SuperAdmin | Admin | User | ReadOnly),
    }
}

/// Whether `caller`'s role permits creating or rotating a hierarchical key
/// at `depth` (1 = ROOT, 2 = INTERMEDIATE, >=3 = OPERATIONAL).
pub fn dominates_depth(caller: Role, depth: u8) -> bool {
    use Role::*;
    match depth {
        1 => matches!(caller, SuperAdmin | BootstrapAdmin),
        2 => matches!(caller, SuperAdmin | Admin | BootstrapAdmin),
        _ => matches!(caller, SuperAdmin | Admin | User | BootstrapAdmin),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Role::*;

    #[test]
    fn super_admin_dominates_everything_but_itself_is_allowed() {
        assert!(dominates(SuperAdmin, SuperAdmin));
        assert!(dominates(SuperAdmin, Admin));
        assert!(dominates(SuperAdmin, User));
        assert!(dominates(SuperAdmin, ReadOnly));
    }

    #[test]
    fn admin_dominates_only_user_and_read_only() {
        assert!(dominates(Admin, User));
        assert!(dominates(Admin, ReadOnly));
        assert!(!dominates(Admin, Admin));
        assert!(!dominates(Admin, SuperAdmin));
    }

    #[test]
    fn user_and_read_only_dominate_nothing() {
        assert!(!dominates(User, ReadOnly));
        assert!(!dominates(ReadOnly, ReadOnly));
    }

    #[test]
    fn depth_matrix_matches_spec() {
        assert!(dominates_depth(SuperAdmin, 1));
        assert!(!dominates_depth(Admin, 1));
        assert!(dominates_depth(Admin, 2));
        assert!(!dominates_depth(User, 2));
        assert!(dominates_depth(User, 3));
        assert!(!dominates_depth(ReadOnly, 3));
    }
}
