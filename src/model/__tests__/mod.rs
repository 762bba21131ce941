mod positional_encoding_test;
