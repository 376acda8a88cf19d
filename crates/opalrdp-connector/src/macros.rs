macro_rules! general_err {
    ( $description:expr $(,)? ) => {{
        <crate::ConnectorError as crate::ConnectorErrorExt>::general($description)
    }};
}

macro_rules! reason_err {
    ( $context:expr, $($arg:tt)* ) => {{
        <crate::ConnectorError as crate::ConnectorErrorExt>::reason($context, format!($($arg)*))
    }};
}

macro_rules! custom_err {
    ( $context:expr, $source:expr $(,)? ) => {{
        <crate::ConnectorError as crate::ConnectorErrorExt>::custom($context, $source)
    }};
}
